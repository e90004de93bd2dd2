// tests/property/main.rs

mod def_use;
mod scheduler;
