pub mod client;

pub use client::SnackClient;
