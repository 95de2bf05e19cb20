pub mod frame;
pub mod primitive;
pub mod request;
pub mod response;
