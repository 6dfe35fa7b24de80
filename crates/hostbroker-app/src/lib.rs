pub mod bus;
pub mod capability;
pub mod commands;
pub mod error;
pub mod events;
pub mod handlers;
pub mod runtime;
pub mod selection;

pub use bus::{CommandBus, QueryBus};
pub use commands::{
    CancelRequestCommand, Command, CommandOutcome, CompleteRequestCommand,
    CreateMachineRequestCommand, CreateReturnRequestCommand, Query, QueryResult,
    ReturnGroupOutcome, ReturnOutcome, SaveTemplateCommand, UpdateRequestStatusCommand,
};
pub use error::AppError;
pub use events::{publish_all, EventPublisher, TracingEventPublisher};
pub use runtime::AppContext;
