pub mod bot;
pub mod feed;
