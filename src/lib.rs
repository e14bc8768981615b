//! A crawler whose pages earn rewards for newly extracted items, with many
//! independent runs crawling side by side without sharing state.

pub mod cli;
pub mod crawler;
pub mod extract;
pub mod goal;
pub mod storage;
pub mod utils;
