pub mod catalog;
pub mod parse;
pub mod regression;
