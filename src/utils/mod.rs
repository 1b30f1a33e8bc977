pub mod json;
pub mod sql_enum;
