pub mod access_validator;
pub mod copy_orchestrator;
pub mod copy_service;
pub mod key_translator;
pub mod storage_service;

#[cfg(test)]
pub(crate) mod memory_store;
