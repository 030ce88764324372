fn main() {
    edgewatch_lib::run()
}
