pub mod archive;
pub mod backup_config;
pub mod coordinator;
pub mod layout;
pub mod naming;
pub mod notifications;
pub mod progress;
pub mod result_error;
pub mod retention;
pub mod scheduler;
pub mod single_flight;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
