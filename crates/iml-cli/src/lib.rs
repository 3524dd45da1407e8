//! Library half of the `iml` command line tool: configuration loading, the
//! explain runner and dataset inspection.
pub mod explain;
pub mod inspect;
pub mod util;
