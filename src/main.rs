fn main() -> anyhow::Result<()> {
    camwatch_lib::run()
}
