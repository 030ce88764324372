use std::{env, net::SocketAddr, path::PathBuf};

use crate::error::ConfigError;

pub const BLOB_ACCOUNT_VAR: &str = "EDGEWATCH_BLOB_ACCOUNT";
pub const BLOB_KEY_VAR: &str = "EDGEWATCH_BLOB_KEY";

/// A command line split on whitespace: program followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn parse(key: &'static str, raw: &str) -> Result<Self, ConfigError> {
        let mut parts = raw.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(ConfigError::Invalid {
            key,
            reason: "command is empty".into(),
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn to_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

#[derive(Debug, Clone)]
pub struct BlobCredentials {
    pub account: String,
    pub key: String,
}

/// Static process configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub credentials: BlobCredentials,
    pub data_dir: PathBuf,
    pub blob_root: PathBuf,
    pub method_addr: SocketAddr,
    pub video_cmd: CommandLine,
    pub still_cmd: CommandLine,
    pub probe_cmd: CommandLine,
    pub classifier_cmd: CommandLine,
    pub categories_path: PathBuf,
    pub installer_cmd: CommandLine,
    pub mp4box: String,
    pub model_blob: String,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::MissingCredential(key))
        };
        let credentials = BlobCredentials {
            account: required(BLOB_ACCOUNT_VAR)?,
            key: required(BLOB_KEY_VAR)?,
        };

        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let command = |key: &'static str, default: &str| CommandLine::parse(key, &or_default(key, default));

        let data_dir = PathBuf::from(or_default("EDGEWATCH_DATA_DIR", "./edgewatch-data"));
        let blob_root = lookup("EDGEWATCH_BLOB_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("blobs"));
        let categories_path = lookup("EDGEWATCH_CATEGORIES")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("categories.txt"));

        let raw_addr = or_default("EDGEWATCH_METHOD_ADDR", "127.0.0.1:7878");
        let method_addr = raw_addr.parse().map_err(|err| ConfigError::Invalid {
            key: "EDGEWATCH_METHOD_ADDR",
            reason: format!("{raw_addr}: {err}"),
        })?;

        Ok(Self {
            credentials,
            blob_root,
            categories_path,
            method_addr,
            video_cmd: command(
                "EDGEWATCH_VIDEO_CMD",
                "rpicam-vid -t 0 -n --inline --width 1280 --height 720 --codec h264 -o -",
            )?,
            still_cmd: command("EDGEWATCH_STILL_CMD", "rpicam-still -n -t 1")?,
            probe_cmd: command("EDGEWATCH_PROBE_CMD", "rpicam-hello --list-cameras")?,
            classifier_cmd: command("EDGEWATCH_CLASSIFIER_CMD", "./pi3/build/classify")?,
            installer_cmd: command("EDGEWATCH_INSTALLER_CMD", "python3 pisetup.py")?,
            mp4box: or_default("EDGEWATCH_MP4BOX", "MP4Box"),
            model_blob: or_default("EDGEWATCH_MODEL_BLOB", "zippedpi3"),
            data_dir,
        })
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.data_dir.join("captures")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.data_dir.join("events")
    }

    pub fn retained_dir(&self) -> PathBuf {
        self.data_dir.join("retained")
    }

    pub fn runtime_config_path(&self) -> PathBuf {
        self.data_dir.join("runtime.json")
    }

    pub fn model_record_path(&self) -> PathBuf {
        self.data_dir.join("updatehistory.json")
    }

    pub fn reported_state_path(&self) -> PathBuf {
        self.data_dir.join("reported.json")
    }
}
