//! External delivery channels for role-change notices.

pub mod email;
