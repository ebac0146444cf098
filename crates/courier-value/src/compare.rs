//! Total ordering and deep equality.
//!
//! Variant tags compare in a fixed order (null < bool < integer < double <
//! string < data < array < dictionary < extensions). A non-negative signed
//! integer compares equal to the same unsigned magnitude, so the sign-
//! neutral range is normalized. Doubles compare by raw bit pattern: NaN
//! equals itself when the bits match, which keeps values dedupable.
//! Containers compare length first, then child by child in order.

use std::cmp::Ordering;

use crate::value::Repr;
use crate::Value;

/// Rank of the variant tag in the fixed comparison order.
fn tag_rank(repr: &Repr) -> u8 {
    match repr {
        Repr::Null => 0,
        Repr::Bool(_) => 1,
        Repr::Int64(_) | Repr::Uint64(_) => 2,
        Repr::Double(_) => 3,
        Repr::String(_) => 4,
        Repr::Data(_) => 5,
        Repr::Array(_) => 6,
        Repr::Dictionary(_) => 7,
        // Extension variants order among themselves by ext kind.
        Repr::Uuid(_) => 8,
        Repr::Date(_) => 9,
        Repr::Fd(_) => 10,
        Repr::SharedMemory(..) => 11,
        Repr::Endpoint(_) => 12,
        Repr::Error(..) => 13,
    }
}

fn integer_cmp(a: &Repr, b: &Repr) -> Ordering {
    // Normalize the sign-neutral range: a non-negative Int64 is the same
    // number as the equal Uint64.
    let (a_neg, a_mag) = match a {
        Repr::Int64(v) if *v < 0 => (true, v.unsigned_abs()),
        Repr::Int64(v) => (false, *v as u64),
        Repr::Uint64(v) => (false, *v),
        _ => return Ordering::Equal,
    };
    let (b_neg, b_mag) = match b {
        Repr::Int64(v) if *v < 0 => (true, v.unsigned_abs()),
        Repr::Int64(v) => (false, *v as u64),
        Repr::Uint64(v) => (false, *v),
        _ => return Ordering::Equal,
    };
    match (a_neg, b_neg) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a_mag.cmp(&b_mag),
        // Both negative: larger magnitude is the smaller number.
        (true, true) => b_mag.cmp(&a_mag),
    }
}

pub(crate) fn value_cmp(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (&a.node.repr, &b.node.repr);

    let rank = tag_rank(ra).cmp(&tag_rank(rb));
    if rank != Ordering::Equal {
        return rank;
    }

    match (ra, rb) {
        (Repr::Null, Repr::Null) => Ordering::Equal,
        (Repr::Bool(x), Repr::Bool(y)) => x.cmp(y),
        (Repr::Int64(_) | Repr::Uint64(_), Repr::Int64(_) | Repr::Uint64(_)) => {
            integer_cmp(ra, rb)
        }
        (Repr::Double(x), Repr::Double(y)) => x.to_bits().cmp(&y.to_bits()),
        (Repr::String(x), Repr::String(y)) => x.as_str().cmp(y.as_str()),
        (Repr::Data(x), Repr::Data(y)) => x.as_ref().cmp(y.as_ref()),
        (Repr::Uuid(x), Repr::Uuid(y)) => x.cmp(y),
        (Repr::Date(x), Repr::Date(y)) => x.cmp(y),
        (Repr::Fd(x), Repr::Fd(y)) => {
            if x.same_slot(y) {
                Ordering::Equal
            } else {
                x.raw_fd().cmp(&y.raw_fd())
            }
        }
        (Repr::SharedMemory(xs, xl), Repr::SharedMemory(ys, yl)) => {
            if xs.same_slot(ys) {
                xl.cmp(yl)
            } else {
                xs.raw_fd().cmp(&ys.raw_fd()).then(xl.cmp(yl))
            }
        }
        (Repr::Endpoint(x), Repr::Endpoint(y)) => x.cmp(y),
        (Repr::Error(xc, xm), Repr::Error(yc, ym)) => xc.cmp(yc).then_with(|| xm.cmp(ym)),
        (Repr::Array(xs), Repr::Array(ys)) => {
            // Length first; the codec relies on this header-level ordering.
            xs.len().cmp(&ys.len()).then_with(|| {
                for (x, y) in xs.iter().zip(ys) {
                    let child = value_cmp(x, y);
                    if child != Ordering::Equal {
                        return child;
                    }
                }
                Ordering::Equal
            })
        }
        (Repr::Dictionary(xs), Repr::Dictionary(ys)) => {
            xs.len().cmp(&ys.len()).then_with(|| {
                for (x, y) in xs.iter().zip(ys) {
                    let key = x.key.as_str().cmp(y.key.as_str());
                    if key != Ordering::Equal {
                        return key;
                    }
                    let child = value_cmp(&x.value, &y.value);
                    if child != Ordering::Equal {
                        return child;
                    }
                }
                Ordering::Equal
            })
        }
        // Distinct tags were handled by the rank comparison above.
        _ => Ordering::Equal,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        value_cmp(self, other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(value_cmp(self, other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        value_cmp(self, other)
    }
}
