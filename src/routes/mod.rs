pub mod maintenance_routes;
pub mod rider_routes;
pub mod vehicle_routes;
