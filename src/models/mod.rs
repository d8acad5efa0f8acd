pub mod assignment;
pub mod courier;
pub mod geofence;
pub mod queue;
