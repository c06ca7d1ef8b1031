pub mod arguments;
pub mod run;
