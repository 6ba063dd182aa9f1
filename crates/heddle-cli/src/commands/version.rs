use miette::Result;

pub fn run() -> Result<()> {
    println!("heddle {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
