pub mod emergency;
pub mod orders;
pub mod protection;
