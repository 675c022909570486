//! Ready-made node modules

pub mod property;

pub use property::PropertyModule;
