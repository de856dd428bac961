use anyhow::Result;

fn main() -> Result<()> {
    querybox::cli::run()
}
