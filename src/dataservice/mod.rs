//! 托管数据服务（Evolver 函数）REST 客户端

pub mod client;

pub use client::DataServiceClient;
