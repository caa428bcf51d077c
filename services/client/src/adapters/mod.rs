pub mod rest;

pub use rest::RestAdapter;
