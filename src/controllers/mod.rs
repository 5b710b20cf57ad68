pub mod maintenance_controller;
pub mod rider_controller;
pub mod vehicle_controller;
