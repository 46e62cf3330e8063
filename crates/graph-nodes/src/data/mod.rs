//! Data nodes
//!
//! Nodes that construct and take apart lists. Both pick their port types
//! at run time.

mod list_item;
mod make_list;

pub use list_item::ListItemNode;
pub use make_list::MakeListNode;
