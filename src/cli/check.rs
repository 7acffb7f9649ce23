use anyhow::Result;

use super::ConfigArgs;

pub fn run_check(args: &ConfigArgs) -> Result<()> {
    println!("HPRO CONFIG CHECK");
    println!();

    let cfg = args.resolve()?;
    super::print_config(&cfg);
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    println!();
    println!("CONFIG OK");
    Ok(())
}
