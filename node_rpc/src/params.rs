//! Positional decoding of request parameters.

use {
    crate::error::RpcError,
    serde::de::DeserializeOwned,
    serde_json::value::RawValue,
};

/// The raw `params` payload of one request, bound positionally against the
/// argument types a handler declares.
///
/// Binding follows the JSON-RPC positional rules: the payload must be an
/// array, extra elements are rejected, and missing trailing elements are
/// read as JSON null so that `Option` arguments default to `None` while
/// required ones fail with `InvalidParams`.
#[derive(Debug, Clone, Default)]
pub struct Params {
    raw: Option<Box<RawValue>>,
    skip: usize,
}

impl Params {
    pub fn new(raw: Option<Box<RawValue>>) -> Self {
        Self { raw, skip: 0 }
    }

    /// Returns the same payload with the first positional element skipped.
    /// Subscribe frames carry the subscription method name there.
    pub fn tail(mut self) -> Self {
        self.skip += 1;
        self
    }

    /// Decodes the payload into the given tuple of argument types.
    pub fn parse<T: ArgList>(&self) -> Result<T, RpcError> {
        let elems = self.positional()?;
        T::bind(&elems)
    }

    /// Decodes a single required argument.
    pub fn one<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        let (value,) = self.parse::<(T,)>()?;
        Ok(value)
    }

    fn positional(&self) -> Result<Vec<&RawValue>, RpcError> {
        let Some(raw) = &self.raw else {
            return Ok(Vec::new());
        };

        let elems: Vec<&RawValue> = serde_json::from_str(raw.get())
            .map_err(|_| RpcError::InvalidParams("non-array params".into()))?;

        Ok(elems.into_iter().skip(self.skip).collect())
    }
}

/// A tuple of positional argument types a handler binds its params against.
pub trait ArgList: Sized {
    const ARITY: usize;

    fn bind(args: &[&RawValue]) -> Result<Self, RpcError>;
}

fn bind_arg<T: DeserializeOwned>(args: &[&RawValue], index: usize) -> Result<T, RpcError> {
    match args.get(index) {
        Some(raw) => serde_json::from_str(raw.get())
            .map_err(|err| RpcError::InvalidParams(format!("invalid argument {index}: {err}"))),
        None => serde_json::from_str("null").map_err(|_| {
            RpcError::InvalidParams(format!("missing value for required argument {index}"))
        }),
    }
}

macro_rules! impl_arg_list {
    ($len:expr $(, $ty:ident : $idx:tt)*) => {
        impl<$($ty: DeserializeOwned),*> ArgList for ($($ty,)*) {
            const ARITY: usize = $len;

            fn bind(args: &[&RawValue]) -> Result<Self, RpcError> {
                if args.len() > $len {
                    return Err(RpcError::InvalidParams(format!(
                        "too many arguments, want at most {}",
                        $len
                    )));
                }

                Ok(($(bind_arg::<$ty>(args, $idx)?,)*))
            }
        }
    };
}

impl_arg_list!(0);
impl_arg_list!(1, T0:0);
impl_arg_list!(2, T0:0, T1:1);
impl_arg_list!(3, T0:0, T1:1, T2:2);
impl_arg_list!(4, T0:0, T1:1, T2:2, T3:3);
impl_arg_list!(5, T0:0, T1:1, T2:2, T3:3, T4:4);
impl_arg_list!(6, T0:0, T1:1, T2:2, T3:3, T4:4, T5:5);
impl_arg_list!(7, T0:0, T1:1, T2:2, T3:3, T4:4, T5:5, T6:6);
impl_arg_list!(8, T0:0, T1:1, T2:2, T3:3, T4:4, T5:5, T6:6, T7:7);

#[cfg(test)]
mod test {
    use super::*;

    fn params(raw: &str) -> Params {
        Params::new(Some(serde_json::value::RawValue::from_string(raw.to_owned()).unwrap()))
    }

    #[test]
    fn binds_positional_arguments() {
        let (s, n, b) = params(r#"["hello",7,true]"#)
            .parse::<(String, u64, bool)>()
            .unwrap();

        assert_eq!(s, "hello");
        assert_eq!(n, 7);
        assert!(b);
    }

    #[test]
    fn missing_trailing_optional_defaults_to_none() {
        let (s, opt) = params(r#"["hello"]"#)
            .parse::<(String, Option<u64>)>()
            .unwrap();

        assert_eq!(s, "hello");
        assert_eq!(opt, None);
    }

    #[test]
    fn missing_required_argument_fails() {
        let err = params(r#"["hello"]"#)
            .parse::<(String, u64)>()
            .unwrap_err();

        assert_eq!(
            err,
            RpcError::InvalidParams("missing value for required argument 1".into())
        );
    }

    #[test]
    fn absent_params_bind_optionals_only() {
        let empty = Params::new(None);

        assert_eq!(empty.parse::<(Option<u64>,)>().unwrap(), (None,));
        assert!(matches!(
            empty.parse::<(u64,)>(),
            Err(RpcError::InvalidParams(_))
        ));
    }

    #[test]
    fn extra_arguments_fail() {
        let err = params(r#"[1,2]"#).parse::<(u64,)>().unwrap_err();

        assert_eq!(
            err,
            RpcError::InvalidParams("too many arguments, want at most 1".into())
        );
    }

    #[test]
    fn non_array_params_fail() {
        let err = params(r#"{"a":1}"#).parse::<(u64,)>().unwrap_err();

        assert_eq!(err, RpcError::InvalidParams("non-array params".into()));
    }

    #[test]
    fn wrong_argument_type_fails() {
        let err = params(r#"["seven"]"#).parse::<(u64,)>().unwrap_err();

        assert!(matches!(err, RpcError::InvalidParams(msg) if msg.starts_with("invalid argument 0")));
    }

    #[test]
    fn tail_skips_the_first_element() {
        let bound = params(r#"["newHeads",3]"#).tail().one::<u64>().unwrap();

        assert_eq!(bound, 3);
    }

    #[test]
    fn unit_binding_rejects_any_argument() {
        assert!(params(r#"[]"#).parse::<()>().is_ok());
        assert!(matches!(
            params(r#"[1]"#).parse::<()>(),
            Err(RpcError::InvalidParams(_))
        ));
    }
}
