pub mod parser;
pub mod tree;
pub mod tui;

pub use parser::{Decoder, LogParser, Message, ParseError, ParseResult, SUPPORTED_VERSION};
pub use tree::{
    Entry, EntryData, ExpandState, FilteredTree, Lease, RunInfo, SessionManager, StatusLevel,
    TreeBuilder, TreeFilter,
};
