use super::*;
use enumset::EnumSet;

impl DType {
    const fn promotion_lattice(self) -> &'static [Self] {
        use DType::*;
        match self {
            Bool => &[Int8, UInt8],
            Int8 => &[Int16],
            Int16 => &[Int32],
            Int32 => &[Int64],
            Int64 => &[Float16, BFloat16],
            UInt8 => &[Int16, UInt16],
            UInt16 => &[Int32, UInt32],
            UInt32 => &[Int64, UInt64],
            UInt64 => &[Float16, BFloat16],
            Float16 => &[Float32],
            BFloat16 => &[Float32],
            Float32 => &[Float64],
            Float64 => &[],
        }
    }

    fn get_recursive_parents(self) -> EnumSet<Self> {
        self.promotion_lattice()
            .iter()
            .fold(EnumSet::only(self), |dtypes, &parent| dtypes.union(parent.get_recursive_parents()))
    }

    /// Find the least upper bound type for a set of dtypes.
    ///
    /// Returns the most specific type every input promotes to, or `None` when
    /// the lattice has no common parent (or the input is empty).
    pub fn least_upper_dtype(dtypes: &[Self]) -> Option<Self> {
        dtypes.iter().map(|d| d.get_recursive_parents()).reduce(|lhs, rhs| lhs.intersection(rhs))?.iter().min()
    }
}
