//! External delivery channels for connection notifications.

pub mod http;
