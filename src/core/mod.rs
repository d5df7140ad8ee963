pub mod codec;
pub mod compiler;
pub mod identity;
pub mod input_descriptor;
pub mod openapi;
pub mod policy;
pub mod presentation_definition;
pub mod proxy;
pub mod resource;
pub mod transport;
pub mod util;
