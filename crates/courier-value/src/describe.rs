//! Human-readable value descriptions, for logging only.

use std::fmt;
use std::fmt::Write;

use crate::value::Repr;
use crate::Value;

impl Value {
    /// Render a line-wrapped description with indentation equal to nesting
    /// depth.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        describe_level(self, &mut out, 0);
        out
    }
}

fn indent(out: &mut String, level: usize) {
    let _ = write!(out, "{:width$}", "", width = level * 4);
}

fn describe_level(value: &Value, out: &mut String, level: usize) {
    let _ = write!(out, "({}) ", value.value_type());

    match &value.node.repr {
        Repr::Dictionary(entries) => {
            out.push('\n');
            for entry in entries {
                indent(out, level + 1);
                let _ = write!(out, "{:?}: ", entry.key.as_str());
                describe_level(&entry.value, out, level + 1);
            }
        }
        Repr::Array(items) => {
            out.push('\n');
            for (index, item) in items.iter().enumerate() {
                indent(out, level + 1);
                let _ = write!(out, "{}: ", index);
                describe_level(item, out, level + 1);
            }
        }
        Repr::Null => out.push_str("<null>\n"),
        Repr::Bool(v) => {
            let _ = writeln!(out, "{}", if *v { "true" } else { "false" });
        }
        Repr::Int64(v) => {
            let _ = writeln!(out, "{}", v);
        }
        Repr::Uint64(v) => {
            let _ = writeln!(out, "{:x}", v);
        }
        Repr::Double(v) => {
            let _ = writeln!(out, "{}", v);
        }
        Repr::String(s) => {
            let _ = writeln!(out, "{:?}", s.as_str());
        }
        Repr::Data(bytes) => {
            let _ = writeln!(out, "<{} bytes>", bytes.len());
        }
        Repr::Uuid(u) => {
            let _ = writeln!(
                out,
                "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
                u[0], u[1], u[2], u[3], u[4], u[5], u[6], u[7],
                u[8], u[9], u[10], u[11], u[12], u[13], u[14], u[15],
            );
        }
        Repr::Date(nanos) => {
            let _ = writeln!(out, "{}", nanos);
        }
        Repr::Fd(slot) => match slot.raw_fd() {
            Some(fd) => {
                let _ = writeln!(out, "<fd {}>", fd);
            }
            None => out.push_str("<fd drained>\n"),
        },
        Repr::SharedMemory(slot, size) => match slot.raw_fd() {
            Some(fd) => {
                let _ = writeln!(out, "<fd {} size {}>", fd, size);
            }
            None => {
                let _ = writeln!(out, "<drained size {}>", size);
            }
        },
        Repr::Endpoint(name) => {
            let _ = writeln!(out, "<{}>", name);
        }
        Repr::Error(code, message) => {
            let _ = writeln!(out, "{}: {}", code, message);
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe().trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_description_indents() {
        let mut dict = Value::dictionary();
        dict.dict_set_int64("answer", 42).unwrap();
        let mut arr = Value::array();
        arr.array_append(Value::string("x")).unwrap();
        dict.dict_set("items", arr).unwrap();

        let text = dict.describe();
        assert!(text.starts_with("(dictionary)"));
        assert!(text.contains("    \"answer\": (int64) 42\n"));
        assert!(text.contains("    \"items\": (array) \n"));
        assert!(text.contains("        0: (string) \"x\"\n"));
    }

    #[test]
    fn uuid_formats_canonically() {
        let v = Value::uuid([
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x12, 0x34, 0x56, 0x78, 0x9a,
            0xbc, 0xde, 0xf0,
        ]);
        assert!(v.describe().contains("12345678-9abc-def0-1234-56789abcdef0"));
    }

    #[test]
    fn drained_fd_is_visible() {
        let v = Value::fd_slot(courier_core::ResourceSlot::empty());
        assert!(v.describe().contains("<fd drained>"));
    }
}
