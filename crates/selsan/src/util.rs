use std::fmt::{self, Display};

macro_rules! try_match {
    ($scrutinee:expr, $pattern:pat => $map:expr) => {
        match $scrutinee {
            $pattern => Some($map),
            _ => None,
        }
    };
}

pub(crate) use try_match;

pub fn format_list<'a, T: Display>(items: &'a [T], conjunction: &'a str) -> impl Display + 'a {
    struct ListFormatter<'a, T> {
        items: &'a [T],
        conjunction: &'a str,
    }

    impl<T: Display> Display for ListFormatter<'_, T> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self.items {
                [] => Ok(()),
                [item] => item.fmt(f),
                [first, second] => write!(f, "{} {} {}", first, self.conjunction, second),

                [first, middle @ .., last] => {
                    write!(f, "{}", first)?;

                    for item in middle {
                        write!(f, ", {}", item)?;
                    }

                    write!(f, ", {} {}", self.conjunction, last)
                }
            }
        }
    }

    ListFormatter { items, conjunction }
}

/// Formats `part` as a percentage of `total`, or `-` if the total is zero.
pub fn format_ratio(part: usize, total: usize) -> impl Display {
    struct RatioFormatter(usize, usize);

    impl Display for RatioFormatter {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self.1 {
                0 => write!(f, "-"),
                total => write!(f, "{:.2}%", self.0 as f64 * 100.0 / total as f64),
            }
        }
    }

    RatioFormatter(part, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_list() {
        assert_eq!(format_list(&["a"], "or").to_string(), "a");
        assert_eq!(format_list(&["a", "b"], "or").to_string(), "a or b");
        assert_eq!(format_list(&["a", "b", "c"], "and").to_string(), "a, b, and c");
    }

    #[test]
    fn test_format_ratio() {
        assert_eq!(format_ratio(1, 3).to_string(), "33.33%");
        assert_eq!(format_ratio(0, 0).to_string(), "-");
    }
}
