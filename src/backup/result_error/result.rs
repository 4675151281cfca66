use crate::backup::result_error::error::Error;
use crate::backup::result_error::{AddDebugObjectAndFnName, AddFunctionName, AddMsg};
use std::fmt::Debug;

pub type Result<T> = std::result::Result<T, Error>;

impl<S: Into<String>, O: Debug + Send + Sync + 'static, R> AddDebugObjectAndFnName<S, O>
    for Result<R>
{
    fn add_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        self.map_err(|e| e.add_debug_object_and_fn_name(obj, fn_name))
    }
}

impl<R, S: Into<String>> AddMsg<S> for Result<R> {
    fn add_msg(self, msg: S) -> Self {
        self.map_err(|e| e.add_msg(msg))
    }
}

impl<R, S: Into<String>> AddFunctionName<S> for Result<R> {
    fn add_fn_name(self, fn_name: S) -> Self {
        self.map_err(|e| e.add_fn_name(fn_name))
    }
}
