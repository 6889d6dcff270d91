pub mod delete_files;
pub mod drain_file;
pub mod list_files;
pub mod put_file;
pub mod read_file;
pub mod replicate_file;
pub mod resync_node;

pub use delete_files::{
    DeleteFilesOperation, DeleteFilesOperationRequest, DeleteFilesOperationResult,
};
pub use drain_file::{DrainFileOperation, DrainFileOperationOutcome, DrainFileOperationRequest};
pub use list_files::{
    ListFileItem, ListFilesOperation, ListFilesOperationRequest, ListFilesOperationResult,
};
pub use put_file::{
    PutFileOperation, PutFileOperationOutcome, PutFileOperationRequest, PutFileOperationResult,
};
pub use read_file::{ReadFileOperation, ReadFileOperationOutcome, ReadFileOperationRequest};
pub use replicate_file::{
    ReplicateFileOperation, ReplicateFileOperationOutcome, ReplicateFileOperationRequest,
};
pub use resync_node::{
    DropHolderOutcome, ResyncNodeOperation, ResyncNodeOperationRequest, ResyncNodeOperationResult,
};
