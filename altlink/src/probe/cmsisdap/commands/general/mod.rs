pub mod connect;
pub mod disconnect;
pub mod host_status;
pub mod info;
