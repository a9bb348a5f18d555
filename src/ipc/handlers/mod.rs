pub mod circulars;
pub mod core;
pub mod gpa;
pub mod marks;
pub mod settings;
pub mod students;
pub mod timetable;
