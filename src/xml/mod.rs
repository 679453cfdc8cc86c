pub mod reader;
pub mod writer;

pub use reader::{open_source, EntryReader};
pub use writer::{
    render_calls, render_messages, render_raw_entries, write_calls_year_file,
    write_messages_year_file,
};
