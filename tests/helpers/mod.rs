#![allow(dead_code)]

pub mod builders;
pub mod files;
pub mod models;

pub use builders::EnforcerFixture;
pub use files::TestFiles;
