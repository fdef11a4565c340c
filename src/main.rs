pub fn main() -> std::process::ExitCode {
    flowrite::run()
}
