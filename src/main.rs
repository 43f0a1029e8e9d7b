use eyre::Result;

use minidb::cli::Repl;
use minidb::Table;

fn main() -> Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "minidb.db".to_string());

    let table = Table::open(&path)?;
    Repl::new(table)?.run()
}
