pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod store;
pub mod tasks {
    pub mod loader;
    pub mod player;
    pub mod viewer;
}
