//! Session-bus coordinates of the guard daemon, shared by server and client.

pub const BUS_NAME: &str = "org.faceid.Guard1";
pub const OBJECT_PATH: &str = "/org/faceid/Guard1";
pub const INTERFACE: &str = "org.faceid.Guard1";
