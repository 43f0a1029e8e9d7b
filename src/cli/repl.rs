//! # REPL - Read-Eval-Print Loop
//!
//! The interactive loop for the minidb shell. Reads input with rustyline,
//! dispatches dot commands and statements, and prints results. Statement
//! errors do not terminate the loop; `.exit` or Ctrl-D closes the database
//! (the durability point) and leaves.

use eyre::{bail, Result, WrapErr};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::btree::{
    INTERNAL_MAX_KEYS, INTERNAL_MIN_KEYS, LEAF_MAX_CELLS, LEAF_MIN_CELLS,
};
use crate::database::Table;
use crate::record::{Row, ROW_SIZE};
use crate::storage::{PAGE_SIZE, TABLE_MAX_PAGES};

const PROMPT: &str = "minidb> ";

pub struct Repl {
    table: Table,
    editor: DefaultEditor,
}

enum LineResult {
    Continue,
    Exit,
}

impl Repl {
    pub fn new(table: Table) -> Result<Self> {
        let editor = DefaultEditor::new().wrap_err("failed to initialize line editor")?;
        Ok(Self { table, editor })
    }

    pub fn run(mut self) -> Result<()> {
        println!("minidb shell. Enter .help for help, .exit to quit.");

        loop {
            match self.editor.readline(PROMPT) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    self.editor.add_history_entry(trimmed).ok();

                    match self.handle_line(trimmed) {
                        Ok(LineResult::Continue) => {}
                        Ok(LineResult::Exit) => break,
                        Err(err) => eprintln!("Error: {}", err),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("Error reading input: {}", err);
                    break;
                }
            }
        }

        self.table.close()?;
        println!("Bye");
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Result<LineResult> {
        if line.starts_with('.') {
            return self.execute_meta_command(line);
        }
        self.execute_statement(line)?;
        Ok(LineResult::Continue)
    }

    fn execute_meta_command(&mut self, line: &str) -> Result<LineResult> {
        match line {
            ".exit" => Ok(LineResult::Exit),
            ".btree" => {
                print!("{}", self.table.structure()?);
                Ok(LineResult::Continue)
            }
            ".constants" => {
                println!("PAGE_SIZE: {}", PAGE_SIZE);
                println!("TABLE_MAX_PAGES: {}", TABLE_MAX_PAGES);
                println!("ROW_SIZE: {}", ROW_SIZE);
                println!("LEAF_MAX_CELLS: {}", LEAF_MAX_CELLS);
                println!("LEAF_MIN_CELLS: {}", LEAF_MIN_CELLS);
                println!("INTERNAL_MAX_KEYS: {}", INTERNAL_MAX_KEYS);
                println!("INTERNAL_MIN_KEYS: {}", INTERNAL_MIN_KEYS);
                Ok(LineResult::Continue)
            }
            ".help" => {
                println!("insert <id> <username> <email>");
                println!("select");
                println!("delete <id>");
                println!(".btree       print the tree structure");
                println!(".constants   print the layout constants");
                println!(".exit        close the database and quit");
                Ok(LineResult::Continue)
            }
            _ => {
                bail!("unrecognized command: '{}'", line);
            }
        }
    }

    fn execute_statement(&mut self, line: &str) -> Result<()> {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        match tokens.as_slice() {
            ["insert", id, username, email] => {
                let id: i32 = id
                    .parse()
                    .wrap_err_with(|| format!("invalid id: '{}'", id))?;
                let row = Row::new(id, username, email)?;
                self.table.insert(&row)?;
                println!("Executed.");
            }
            ["select"] => {
                let rows = self.table.scan()?;
                for row in &rows {
                    println!("({}, {}, {})", row.id(), row.username()?, row.email()?);
                }
                println!(
                    "{} row{} in set",
                    rows.len(),
                    if rows.len() == 1 { "" } else { "s" }
                );
            }
            ["delete", id] => {
                let id: i32 = id
                    .parse()
                    .wrap_err_with(|| format!("invalid id: '{}'", id))?;
                self.table.delete(id)?;
                println!("Executed.");
            }
            _ => bail!("unrecognized statement: '{}'", line),
        }

        Ok(())
    }
}
