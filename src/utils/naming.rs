use chrono::{DateTime, Utc};

use crate::models::SegmentKind;

/// UTC stamp embedded in every artifact name. Lexical order equals
/// chronological order.
pub fn stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

pub fn still_name(captured_at: DateTime<Utc>) -> String {
    format!("image-{}.jpg", stamp(captured_at))
}

pub fn raw_segment_name(kind: SegmentKind, event_start: DateTime<Utc>) -> String {
    format!("video-{}-{}.h264", kind.as_str(), stamp(event_start))
}

pub fn playable_segment_name(kind: SegmentKind, event_start: DateTime<Utc>) -> String {
    format!("video-{}-{}.mp4", kind.as_str(), stamp(event_start))
}

pub fn full_clip_name(event_start: DateTime<Utc>) -> String {
    format!("video-full-{}.mp4", stamp(event_start))
}

pub fn descriptor_name(event_start: DateTime<Utc>) -> String {
    format!("video-description-{}.json", stamp(event_start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn names_embed_utc_stamp_and_role() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();

        assert_eq!(stamp(at), "20240309070501");
        assert_eq!(still_name(at), "image-20240309070501.jpg");
        assert_eq!(
            raw_segment_name(SegmentKind::Before, at),
            "video-before-20240309070501.h264"
        );
        assert_eq!(
            playable_segment_name(SegmentKind::After, at),
            "video-after-20240309070501.mp4"
        );
        assert_eq!(full_clip_name(at), "video-full-20240309070501.mp4");
        assert_eq!(descriptor_name(at), "video-description-20240309070501.json");
    }

    #[test]
    fn stamps_sort_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert!(full_clip_name(earlier) < full_clip_name(later));
    }
}
