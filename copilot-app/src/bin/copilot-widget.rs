pub fn main() {
    copilot_app::app::launch();
}
