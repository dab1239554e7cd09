pub mod classes;
pub mod core;
pub mod marks;
pub mod sessions;
pub mod students;
pub mod subjects;
pub mod teachers;
pub mod users;
