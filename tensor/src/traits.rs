use crate::LazyTensor;

/// Implements a binary operator trait for every ownership combination,
/// forwarding to the `try_*` method.
macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $try_method:ident, $error_msg:expr) => {
        impl std::ops::$trait for &LazyTensor {
            type Output = LazyTensor;

            #[track_caller]
            fn $method(self, other: &LazyTensor) -> LazyTensor {
                self.$try_method(other).expect($error_msg)
            }
        }

        impl std::ops::$trait for LazyTensor {
            type Output = LazyTensor;

            #[track_caller]
            fn $method(self, other: LazyTensor) -> LazyTensor {
                (&self).$method(&other)
            }
        }

        impl std::ops::$trait<LazyTensor> for &LazyTensor {
            type Output = LazyTensor;

            #[track_caller]
            fn $method(self, other: LazyTensor) -> LazyTensor {
                self.$method(&other)
            }
        }

        impl std::ops::$trait<&LazyTensor> for LazyTensor {
            type Output = LazyTensor;

            #[track_caller]
            fn $method(self, other: &LazyTensor) -> LazyTensor {
                (&self).$method(other)
            }
        }
    };
}

impl_binary_op!(Add, add, try_add, "addition failed");
impl_binary_op!(Sub, sub, try_sub, "subtraction failed");
impl_binary_op!(Mul, mul, try_mul, "multiplication failed");
impl_binary_op!(Div, div, try_div, "division failed");

impl std::ops::Neg for &LazyTensor {
    type Output = LazyTensor;

    #[track_caller]
    fn neg(self) -> LazyTensor {
        self.try_neg().expect("negation failed")
    }
}

impl std::ops::Neg for LazyTensor {
    type Output = LazyTensor;

    #[track_caller]
    fn neg(self) -> LazyTensor {
        (&self).neg()
    }
}
