//! `JavaVM` invoke interface.

use crate::{
    emulation::{
        engine::{ReturnValue, TrapAction},
        runtime::{
            jni::functions::{InvokeFunction, JNI_ERR, JNI_EVERSION, JNI_OK},
            state::HostContext,
        },
    },
    Result,
};

/// JNI versions `GetEnv` accepts.
const SUPPORTED_VERSIONS: [u32; 5] = [0x0001_0001, 0x0001_0002, 0x0001_0004, 0x0001_0006, 0x0001_0008];

/// Services the invoke interface function `function`.
///
/// There is a single emulated thread, permanently attached: attaching and
/// `GetEnv` hand out the session's `JNIEnv*`.
pub(crate) fn call(ctx: &mut HostContext<'_>, function: InvokeFunction) -> Result<TrapAction> {
    let status = match function {
        InvokeFunction::DestroyJavaVM | InvokeFunction::DetachCurrentThread => JNI_OK,
        InvokeFunction::AttachCurrentThread | InvokeFunction::AttachCurrentThreadAsDaemon => {
            write_env(ctx)?
        }
        InvokeFunction::GetEnv => {
            let version = ctx.arg(2) as u32;
            if SUPPORTED_VERSIONS.contains(&version) {
                write_env(ctx)?
            } else {
                log::debug!("GetEnv for unsupported JNI version {version:#x}");
                JNI_EVERSION
            }
        }
        InvokeFunction::Reserved0 | InvokeFunction::Reserved1 | InvokeFunction::Reserved2 => {
            JNI_ERR
        }
    };
    Ok(TrapAction::Return(ReturnValue::Int(status as i64 as u64)))
}

fn write_env(ctx: &mut HostContext<'_>) -> Result<i32> {
    let out = ctx.arg(1);
    if out == 0 {
        return Ok(JNI_ERR);
    }
    let env = ctx.state.jni_env();
    ctx.memory.write_u64(out, env)?;
    Ok(JNI_OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{emulation::runtime::dispatch::DispatchTable, test::TestRuntime};

    #[test]
    fn test_get_env() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let out = rt.alloc(8);
        assert_eq!(
            rt.invoke(InvokeFunction::GetEnv, &[out, 0x0001_0006]),
            TrapAction::Return(ReturnValue::Int(0))
        );
        assert_eq!(rt.memory.read_u64(out).unwrap(), rt.state.jni_env());
    }

    #[test]
    fn test_get_env_rejects_unknown_version() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let out = rt.alloc(8);
        assert_eq!(
            rt.invoke(InvokeFunction::GetEnv, &[out, 0x0002_0000]),
            TrapAction::Return(ReturnValue::Int(JNI_EVERSION as i64 as u64))
        );
        assert_eq!(rt.memory.read_u64(out).unwrap(), 0);
    }

    #[test]
    fn test_attach_current_thread() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let out = rt.alloc(8);
        assert_eq!(
            rt.invoke(InvokeFunction::AttachCurrentThread, &[out, 0]),
            TrapAction::Return(ReturnValue::Int(0))
        );
        assert_eq!(rt.memory.read_u64(out).unwrap(), rt.state.jni_env());
        assert_eq!(
            rt.invoke(InvokeFunction::DetachCurrentThread, &[]),
            TrapAction::Return(ReturnValue::Int(0))
        );
    }
}
