pub mod rider_repository;
pub mod vehicle_repository;
