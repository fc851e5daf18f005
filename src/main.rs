use sush::Shell;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut shell = Shell::new()?;
    shell.run_startup_rc();
    shell.repl()?;
    Ok(())
}
