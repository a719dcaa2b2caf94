pub mod error;
pub mod index;
pub mod store;

pub mod layout {
    pub mod geometry;
    pub mod meta;
    pub mod path;
    pub mod region;
    pub mod types;
}

pub mod api {
    pub mod image_io;
    pub mod registry;
}
