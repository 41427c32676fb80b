//! 网络层：用 awc 拉取数据，并在协调器移动文件时跟随
mod fetcher;
mod transfers;

pub use fetcher::{create_info, FetchRequest, Fetcher};
pub use transfers::{NetFileHandler, Transfers};
