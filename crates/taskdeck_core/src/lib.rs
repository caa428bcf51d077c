pub mod domain;
pub mod ports;
pub mod validate;

pub use domain::{
    NewTask, Session, SessionChange, SignupOutcome, Task, TaskPatch, TaskStatus, User,
};
pub use ports::{AuthService, PortError, PortResult, SessionChangeStream, TaskService};
pub use validate::ValidationError;
