//! # minidb CLI Module
//!
//! Interactive shell for a minidb database file. This is a consumer of the
//! engine's public API, not part of it: the statement grammar and output
//! format below are shell concerns.
//!
//! ## Statements
//!
//! ```text
//! insert <id> <username> <email>
//! select
//! delete <id>
//! ```
//!
//! ## Dot Commands
//!
//! | Command      | Description                           |
//! |--------------|---------------------------------------|
//! | `.exit`      | Close the database and quit           |
//! | `.btree`     | Print the tree structure              |
//! | `.constants` | Print the derived layout constants    |
//! | `.help`      | Show available commands               |
//!
//! Statement errors (duplicate key, key not found, malformed input) are
//! printed and the loop continues; `.exit` or Ctrl-D closes the table,
//! which is when changes become durable.

pub mod repl;

pub use repl::Repl;
