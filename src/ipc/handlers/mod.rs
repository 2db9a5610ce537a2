pub mod admin;
pub mod bulk;
pub mod classes;
pub mod core;
pub mod divisions;
pub mod exams;
pub mod marks;
pub mod portal;
pub mod session;
pub mod students;
pub mod subjects;
pub mod users;
