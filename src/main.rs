fn main() {
    stories_lib::run()
}
