pub mod ingester;
pub mod rpc;
pub mod scanner;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;
