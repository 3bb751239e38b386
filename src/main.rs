fn main() -> anyhow::Result<()> {
    gateledger::run()?;
    Ok(())
}
