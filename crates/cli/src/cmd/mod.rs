pub mod track;
pub mod users;
