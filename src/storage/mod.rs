pub mod descriptor_store;
pub mod registry;

pub use descriptor_store::{DescriptorBatch, DescriptorStore};
pub use registry::{Employee, EmployeeRegistry, Roster};
