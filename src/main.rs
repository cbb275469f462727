fn main() -> anyhow::Result<()> {
    coleta_lib::run()
}
