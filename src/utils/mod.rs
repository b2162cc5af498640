// Stateless helpers shared by forms and views

pub mod format;
pub mod validation;
