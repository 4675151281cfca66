pub mod archive;
pub mod backup_config;
pub mod compress;
pub mod destination;
pub mod dump;
pub mod events;
pub mod file_ext;
pub mod finish;
pub mod job;
pub mod manifest;
pub mod path;
pub mod redacted;
pub mod result_error;
pub mod selection;
pub mod validate;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
