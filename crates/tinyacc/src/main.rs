use anyhow::{Context, Result};
use tinyacc::{countdown_demo, Program, Runner};

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let program = match args.next() {
        Some(path) => {
            log::info!("Loading encoded program '{}'", path);
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read program file '{}'", path))?;
            Program::from_bytes(&bytes)?
        }
        None => {
            log::info!("No program file given, running the bundled countdown demo");
            countdown_demo()
        }
    };

    let mut runner = Runner::new(program);
    let summary = runner.run()?;

    println!("steps executed: {}", summary.steps);
    println!(
        "A = {}, B = {}, ACC = {}",
        summary.registers.a, summary.registers.b, summary.registers.acc
    );
    Ok(())
}
