pub mod partition_storage;
