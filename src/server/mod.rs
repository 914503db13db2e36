pub mod frame;
pub mod protocol;
pub mod operator;
pub mod tcp;
