//! # End-to-End Parse Scenarios
//!
//! This test file is the source of truth for reader correctness over small,
//! literal inputs. It covers:
//!
//! - Type inference and the promotion lattice (Int64 → Float64 → String)
//! - Missing sentinels and the missing flag
//! - Quoting, escapes, and embedded newlines
//! - Layout options: headers, data rows, comments, footers, limits
//! - Lexical options: delimiters, decimals, bool strings, date formats
//! - String pooling and ref tables
//! - Warnings and strict mode
//!
//! If a test fails after a change, the reader regressed; do not adjust the
//! expected values.

use std::borrow::Cow;
use std::io::Write;

use tapecsv::{
    parse_bytes, parse_path, Column, File, LogicalType, ReaderOptions, Source, Value,
};

fn parse(data: &str) -> File {
    parse_bytes(data, ReaderOptions::default()).unwrap()
}

fn parse_with(data: &str, opts: ReaderOptions) -> File {
    parse_bytes(data, opts).unwrap()
}

fn string_of(v: Value<'_>) -> String {
    v.as_str().expect("expected a string cell").to_string()
}

mod inference {
    use super::*;

    #[test]
    fn int_float_string_columns() {
        let file = parse("a,b,c\n1,2.0,x\n3,4,y\n");
        assert_eq!(file.names(), ["a", "b", "c"]);
        assert_eq!(file.rows(), 2);
        assert_eq!(file.types()[0].kind, LogicalType::Int64);
        assert_eq!(file.types()[1].kind, LogicalType::Float64);
        assert_eq!(file.types()[2].kind, LogicalType::String);

        // Column b promoted Int64 → Float64: row 1's "4" reads as 4.0.
        assert_eq!(file.get(0, 0), Value::Int(1));
        assert_eq!(file.get(1, 0), Value::Float(2.0));
        assert_eq!(file.get(2, 0), Value::Str(Cow::Borrowed("x")));
        assert_eq!(file.get(0, 1), Value::Int(3));
        assert_eq!(file.get(1, 1), Value::Float(4.0));
        assert_eq!(file.get(2, 1), Value::Str(Cow::Borrowed("y")));
    }

    #[test]
    fn promotion_to_string_preserves_literals() {
        let file = parse("a\n42\n43\nhello\n");
        assert_eq!(file.types()[0].kind, LogicalType::String);
        assert_eq!(string_of(file.get(0, 0)), "42");
        assert_eq!(string_of(file.get(0, 1)), "43");
        assert_eq!(string_of(file.get(0, 2)), "hello");
    }

    #[test]
    fn bool_column() {
        let file = parse("flag\ntrue\nFALSE\nTrue\n");
        assert_eq!(file.types()[0].kind, LogicalType::Bool);
        assert_eq!(file.get(0, 0), Value::Bool(true));
        assert_eq!(file.get(0, 1), Value::Bool(false));
        assert_eq!(file.get(0, 2), Value::Bool(true));
    }

    #[test]
    fn date_and_datetime_columns() {
        let file = parse("d,dt,t\n2024-01-15,2024-01-15T13:45:30,13:45:30\n");
        assert_eq!(file.types()[0].kind, LogicalType::Date);
        assert_eq!(file.types()[1].kind, LogicalType::DateTime);
        assert_eq!(file.types()[2].kind, LogicalType::Time);

        assert_eq!(file.get(0, 0), Value::Date(19737));
        let micros = (13 * 3600 + 45 * 60 + 30) * 1_000_000i64;
        assert_eq!(file.get(1, 0), Value::DateTime(19737 * 86_400_000_000 + micros));
        assert_eq!(file.get(2, 0), Value::Time(micros));
    }

    #[test]
    fn custom_date_format() {
        let opts = ReaderOptions::builder().date_format("dd/mm/yyyy").build().unwrap();
        let file = parse_with("d\n15/01/2024\n16/01/2024\n", opts);
        assert_eq!(file.types()[0].kind, LogicalType::Date);
        assert_eq!(file.get(0, 0), Value::Date(19737));
        assert_eq!(file.get(0, 1), Value::Date(19738));
    }

    #[test]
    fn mixed_date_and_int_becomes_string() {
        let file = parse("a\n2024-01-15\n42\n");
        assert_eq!(file.types()[0].kind, LogicalType::String);
        assert_eq!(string_of(file.get(0, 0)), "2024-01-15");
        assert_eq!(string_of(file.get(0, 1)), "42");
    }

    #[test]
    fn pinned_types_disable_inference() {
        let opts = ReaderOptions::builder()
            .column_type("a", LogicalType::Float64)
            .build()
            .unwrap();
        let file = parse_with("a,b\n1,2\n3,4\n", opts);
        assert_eq!(file.types()[0].kind, LogicalType::Float64);
        assert_eq!(file.types()[1].kind, LogicalType::Int64);
        assert_eq!(file.get(0, 0), Value::Float(1.0));
    }

    #[test]
    fn type_map_rewrites_inference() {
        let opts = ReaderOptions::builder()
            .type_map(LogicalType::Int64, LogicalType::Float64)
            .build()
            .unwrap();
        let file = parse_with("a\n1\n2\n", opts);
        assert_eq!(file.types()[0].kind, LogicalType::Float64);
        assert_eq!(file.get(0, 0), Value::Float(1.0));
    }

    #[test]
    fn reparse_is_idempotent() {
        let data = "a,b,c\n1,2.5,x\n,NA,\n3,4.5,z\n";
        let opts = || ReaderOptions::builder().missing_strings(["", "NA"]).build().unwrap();
        let one = parse_bytes(data, opts()).unwrap();
        let two = parse_bytes(data, opts()).unwrap();

        assert_eq!(one.names(), two.names());
        assert_eq!(one.types(), two.types());
        assert_eq!(one.rows(), two.rows());
        for col in 0..one.cols() {
            for row in 0..one.rows() {
                assert_eq!(one.get(col, row), two.get(col, row));
            }
        }
    }
}

mod missing {
    use super::*;

    #[test]
    fn empty_fields_are_missing_by_default() {
        let file = parse("a,b\n1,hi\n,\n3,bye\n");
        assert_eq!(file.rows(), 3);
        assert_eq!(file.types()[0].kind, LogicalType::Int64);
        assert!(file.types()[0].missing);
        assert_eq!(file.types()[1].kind, LogicalType::String);
        assert!(file.types()[1].missing);

        assert_eq!(file.get(0, 0), Value::Int(1));
        assert_eq!(string_of(file.get(1, 0)), "hi");
        assert_eq!(file.get(0, 1), Value::Missing);
        assert_eq!(file.get(1, 1), Value::Missing);
        assert_eq!(file.get(0, 2), Value::Int(3));
        assert_eq!(string_of(file.get(1, 2)), "bye");
    }

    #[test]
    fn custom_sentinels() {
        let opts = ReaderOptions::builder().missing_strings(["NA", "n/a"]).build().unwrap();
        let file = parse_with("a\n1\nNA\nn/a\n4\n", opts);
        assert_eq!(file.types()[0].kind, LogicalType::Int64);
        assert!(file.types()[0].missing);
        assert_eq!(file.get(0, 1), Value::Missing);
        assert_eq!(file.get(0, 2), Value::Missing);
        assert_eq!(file.get(0, 3), Value::Int(4));
    }

    #[test]
    fn all_missing_column_reads_missing() {
        let opts = ReaderOptions::builder().missing_strings(["NA"]).build().unwrap();
        let file = parse_with("a,b\nNA,1\nNA,2\n", opts);
        assert!(file.types()[0].missing);
        assert_eq!(file.get(0, 0), Value::Missing);
        assert_eq!(file.get(0, 1), Value::Missing);
    }

    #[test]
    fn sentinel_without_missing_column_elsewhere() {
        // Column b never sees a sentinel and carries no missing flag.
        let file = parse("a,b\n,1\n,2\n");
        assert!(file.types()[0].missing);
        assert!(!file.types()[1].missing);
    }
}

mod quoting {
    use super::*;

    #[test]
    fn doubled_quotes_unescape() {
        let file = parse("a\n\"he said \"\"hi\"\"\"\nok\n");
        assert_eq!(file.names(), ["a"]);
        assert_eq!(file.types()[0].kind, LogicalType::String);
        assert_eq!(string_of(file.get(0, 0)), "he said \"hi\"");
        assert_eq!(string_of(file.get(0, 1)), "ok");
    }

    #[test]
    fn embedded_newlines_and_delimiters() {
        let file = parse("a,b\n\"x\ny\",\"1,2\"\nplain,3\n");
        assert_eq!(file.rows(), 2);
        assert_eq!(string_of(file.get(0, 0)), "x\ny");
        assert_eq!(string_of(file.get(1, 0)), "1,2");
        assert_eq!(string_of(file.get(0, 1)), "plain");
    }

    #[test]
    fn distinct_escape_byte() {
        let opts = ReaderOptions::builder().escape(b'\\').build().unwrap();
        let file = parse_with("a\n\"x\\\"y\"\n", opts);
        assert_eq!(string_of(file.get(0, 0)), "x\"y");
    }

    #[test]
    fn custom_quote_byte() {
        let opts = ReaderOptions::builder().quote(b'\'').build().unwrap();
        let file = parse_with("a,b\n'1,5',2\n", opts);
        assert_eq!(string_of(file.get(0, 0)), "1,5");
        assert_eq!(file.get(1, 0), Value::Int(2));
    }

    #[test]
    fn unterminated_quote_is_fatal() {
        let err = parse_bytes("a\n\"open\n", ReaderOptions::default()).unwrap_err();
        assert!(err.to_string().contains("invalid quoted field"));
    }

    #[test]
    fn quoted_numbers_still_infer() {
        let file = parse("a\n\"1\"\n\"2\"\n");
        assert_eq!(file.types()[0].kind, LogicalType::Int64);
        assert_eq!(file.get(0, 0), Value::Int(1));
    }
}

mod layout_options {
    use super::*;

    #[test]
    fn bom_is_consumed() {
        let mut data = vec![0xEF, 0xBB, 0xBF];
        data.extend_from_slice(b"a,b\n1,2\n");
        let file = parse_bytes(data, ReaderOptions::default()).unwrap();
        assert_eq!(file.names(), ["a", "b"]);
        assert_eq!(file.rows(), 1);
        assert_eq!(file.get(0, 0), Value::Int(1));
        assert_eq!(file.get(1, 0), Value::Int(2));
    }

    #[test]
    fn no_header_gives_synthetic_names() {
        let opts = ReaderOptions::builder().no_header().build().unwrap();
        let file = parse_with("1,2\n3,4\n", opts);
        assert_eq!(file.names(), ["Column1", "Column2"]);
        assert_eq!(file.rows(), 2);
    }

    #[test]
    fn explicit_names() {
        let opts = ReaderOptions::builder().header_names(["x", "y"]).build().unwrap();
        let file = parse_with("1,2\n3,4\n", opts);
        assert_eq!(file.names(), ["x", "y"]);
        assert_eq!(file.rows(), 2);
        assert_eq!(file.get(0, 1), Value::Int(3));
    }

    #[test]
    fn header_row_and_data_row() {
        let opts = ReaderOptions::builder().header_row(2).data_row(4).build().unwrap();
        let file = parse_with("preamble\na,b\nunits,kg\n1,2\n", opts);
        assert_eq!(file.names(), ["a", "b"]);
        assert_eq!(file.rows(), 1);
        assert_eq!(file.get(0, 0), Value::Int(1));
    }

    #[test]
    fn header_after_data_is_config_error() {
        let err = ReaderOptions::builder().header_row(5).data_row(2).build().unwrap_err();
        assert!(err.to_string().contains("is not before data row"));
    }

    #[test]
    fn comment_lines_skipped_everywhere() {
        let opts = ReaderOptions::builder().comment("#").build().unwrap();
        let file = parse_with("# generated\na,b\n1,2\n# middle\n3,4\n", opts);
        assert_eq!(file.names(), ["a", "b"]);
        assert_eq!(file.rows(), 2);
        assert_eq!(file.get(0, 1), Value::Int(3));
    }

    #[test]
    fn footer_skip_drops_trailer() {
        let opts = ReaderOptions::builder().footer_skip(1).build().unwrap();
        let file = parse_with("a,b\n1,2\n3,4\ntotal,6\n", opts);
        assert_eq!(file.rows(), 2);
        assert_eq!(file.types()[0].kind, LogicalType::Int64);
        assert_eq!(file.get(0, 1), Value::Int(3));
    }

    #[test]
    fn limit_caps_rows() {
        let opts = ReaderOptions::builder().limit(2).build().unwrap();
        let file = parse_with("a\n1\n2\n3\n4\n", opts);
        assert_eq!(file.rows(), 2);
    }

    #[test]
    fn normalized_duplicate_names() {
        let opts = ReaderOptions::builder().normalize_names(true).build().unwrap();
        let file = parse_with("col a,col a,2x\n1,2,3\n", opts);
        assert_eq!(file.names(), ["col_a", "col_a_1", "_2x"]);
    }

    #[test]
    fn transpose_reads_lines_as_columns() {
        let opts = ReaderOptions::builder().transpose(true).build().unwrap();
        let file = parse_with("id,1,2,3\nname,ann,bob,cal\n", opts);
        assert_eq!(file.names(), ["id", "name"]);
        assert_eq!(file.rows(), 3);
        assert_eq!(file.types()[0].kind, LogicalType::Int64);
        assert_eq!(file.get(0, 2), Value::Int(3));
        assert_eq!(string_of(file.get(1, 1)), "bob");
    }

    #[test]
    fn select_keeps_only_named_columns() {
        let opts = ReaderOptions::builder().select_names(["a", "c"]).build().unwrap();
        let file = parse_with("a,b,c\n1,2,3\n", opts);
        assert_eq!(file.names(), ["a", "c"]);
        assert_eq!(file.get(0, 0), Value::Int(1));
        assert_eq!(file.get(1, 0), Value::Int(3));
    }
}

mod lexical_options {
    use super::*;

    #[test]
    fn semicolon_and_pipe_delimiters() {
        let opts = ReaderOptions::builder().delimiter(b';').build().unwrap();
        let file = parse_with("a;b\n1;2\n", opts);
        assert_eq!(file.get(1, 0), Value::Int(2));

        let file = parse("a|b\n1|2\n3|4\n");
        assert_eq!(file.names(), ["a", "b"]);
        assert_eq!(file.get(1, 1), Value::Int(4));
    }

    #[test]
    fn multi_byte_delimiter() {
        let opts = ReaderOptions::builder().delimiter_str("::").build().unwrap();
        let file = parse_with("a::b\n1::2\n", opts);
        assert_eq!(file.names(), ["a", "b"]);
        assert_eq!(file.get(0, 0), Value::Int(1));
        assert_eq!(file.get(1, 0), Value::Int(2));
    }

    #[test]
    fn repeated_delimiters_collapse() {
        let opts = ReaderOptions::builder()
            .delimiter(b' ')
            .ignore_repeated(true)
            .build()
            .unwrap();
        let file = parse_with("a b\n1   2\n3  4\n", opts);
        assert_eq!(file.names(), ["a", "b"]);
        assert_eq!(file.get(0, 0), Value::Int(1));
        assert_eq!(file.get(1, 1), Value::Int(4));
    }

    #[test]
    fn custom_decimal_byte() {
        let opts = ReaderOptions::builder().delimiter(b';').decimal(b',').build().unwrap();
        let file = parse_with("x\n1,5\n2,5\n", opts);
        assert_eq!(file.types()[0].kind, LogicalType::Float64);
        assert_eq!(file.get(0, 0), Value::Float(1.5));
    }

    #[test]
    fn custom_bool_strings() {
        let opts = ReaderOptions::builder()
            .true_strings(["yes"])
            .false_strings(["no"])
            .build()
            .unwrap();
        let file = parse_with("ok\nyes\nno\n", opts);
        assert_eq!(file.types()[0].kind, LogicalType::Bool);
        assert_eq!(file.get(0, 0), Value::Bool(true));
        assert_eq!(file.get(0, 1), Value::Bool(false));
    }

    #[test]
    fn whitespace_trimmed_around_values() {
        let file = parse("a,b\n  1  , x \n");
        assert_eq!(file.get(0, 0), Value::Int(1));
        assert_eq!(string_of(file.get(1, 0)), "x");
    }
}

mod pooling {
    use super::*;

    #[test]
    fn pooled_refs_deduplicate() {
        let opts = ReaderOptions::builder().pool(true).build().unwrap();
        let file = parse_with("a,b\n1,2\n1,2\n1,2\n", opts);
        assert!(file.types()[0].pooled);
        assert!(file.types()[1].pooled);

        let refs_a = file.pool_refs(0).unwrap();
        assert_eq!(refs_a.len(), 1);
        assert_eq!(&*refs_a[0], b"1");
        let refs_b = file.pool_refs(1).unwrap();
        assert_eq!(refs_b.len(), 1);
        assert_eq!(&*refs_b[0], b"2");

        let Column::Pooled(col) = file.column(0) else { panic!("expected pooled") };
        for row in 0..3 {
            assert_eq!(col.get_ref(row), 1);
            assert_eq!(col.get(row).unwrap(), "1");
        }
    }

    #[test]
    fn pool_bijection_with_escapes() {
        let opts = ReaderOptions::builder().pool(true).build().unwrap();
        let file = parse_with("a\n\"x\"\"y\"\nplain\n\"x\"\"y\"\n", opts);
        let Column::Pooled(col) = file.column(0) else { panic!("expected pooled") };
        assert_eq!(col.refs().len(), 2);
        assert_eq!(col.get(0).unwrap(), "x\"y");
        assert_eq!(col.get(1).unwrap(), "plain");
        assert_eq!(col.get_ref(2), col.get_ref(0));
    }

    #[test]
    fn missing_cells_keep_ref_zero() {
        let opts = ReaderOptions::builder().pool(true).build().unwrap();
        let file = parse_with("a\nx\n\ny\n", opts);
        let opts2 = ReaderOptions::builder()
            .pool(true)
            .ignore_empty_lines(false)
            .build()
            .unwrap();
        let file2 = parse_with("a\nx\n\ny\n", opts2);
        // Empty lines are skipped by default; keeping them yields a missing
        // cell with ref 0.
        assert_eq!(file.rows(), 2);
        assert_eq!(file2.rows(), 3);
        let Column::Pooled(col) = file2.column(0) else { panic!("expected pooled") };
        assert_eq!(col.get_ref(1), 0);
        assert!(col.get(1).is_none());
    }

    #[test]
    fn low_threshold_promotes_to_plain_strings() {
        let opts = ReaderOptions::builder().pool_fraction(0.01).build().unwrap();
        let mut data = String::from("a\n");
        for i in 0..200 {
            data.push_str(&format!("value{}\n", i));
        }
        let file = parse_with(&data, opts);
        assert_eq!(file.types()[0].kind, LogicalType::String);
        assert!(!file.types()[0].pooled);
        assert_eq!(string_of(file.get(0, 199)), "value199");
    }
}

mod warnings_and_errors {
    use super::*;

    #[test]
    fn short_rows_fill_missing_with_warning() {
        let file = parse("a,b,c\n1,2,3\n4\n5,6,7\n");
        assert_eq!(file.rows(), 3);
        assert_eq!(file.get(0, 1), Value::Int(4));
        assert_eq!(file.get(1, 1), Value::Missing);
        assert_eq!(file.get(2, 1), Value::Missing);
        assert!(file.types()[1].missing);
        assert_eq!(file.warnings().len(), 1);
        assert!(file.warnings()[0].message.contains("expected 3 fields, found 1"));
    }

    #[test]
    fn long_rows_truncate_with_warning() {
        let file = parse("a,b\n1,2,3,4\n5,6\n");
        assert_eq!(file.cols(), 2);
        assert_eq!(file.rows(), 2);
        assert_eq!(file.get(0, 0), Value::Int(1));
        assert_eq!(file.get(1, 0), Value::Int(2));
        assert_eq!(file.get(0, 1), Value::Int(5));
        assert_eq!(file.warnings().len(), 1);
        assert!(file.warnings()[0].message.contains("found 4"));
    }

    #[test]
    fn warning_cap_appends_suppression_marker() {
        let opts = ReaderOptions::builder().max_warnings(2).build().unwrap();
        let file = parse_with("a,b\n1\n2\n3\n4\n5\n", opts);
        assert_eq!(file.warnings().len(), 3);
        assert!(file.warnings()[2].message.contains("suppressed"));
    }

    #[test]
    fn silence_warnings_collects_nothing() {
        let opts = ReaderOptions::builder().silence_warnings(true).build().unwrap();
        let file = parse_with("a,b\n1\n2\n", opts);
        assert!(file.warnings().is_empty());
    }

    #[test]
    fn strict_mode_aborts_on_pinned_mismatch() {
        let opts = ReaderOptions::builder()
            .column_type("a", LogicalType::Int64)
            .strict(true)
            .build()
            .unwrap();
        let err = parse_bytes("a\n1\nnope\n", opts).unwrap_err();
        assert!(err.to_string().starts_with("strict parse error:"));
    }

    #[test]
    fn non_strict_pinned_mismatch_is_missing() {
        let opts = ReaderOptions::builder()
            .column_type("a", LogicalType::Int64)
            .build()
            .unwrap();
        let file = parse_bytes("a\n1\nnope\n3\n", opts).unwrap();
        assert_eq!(file.get(0, 0), Value::Int(1));
        assert_eq!(file.get(0, 1), Value::Missing);
        assert_eq!(file.get(0, 2), Value::Int(3));
        assert_eq!(file.warnings().len(), 1);
    }

    #[test]
    fn unknown_pinned_column_is_config_error() {
        let opts = ReaderOptions::builder()
            .column_type("ghost", LogicalType::Int64)
            .build()
            .unwrap();
        let err = parse_bytes("a\n1\n", opts).unwrap_err();
        assert!(err.to_string().starts_with("invalid type:"));
    }
}

mod sources {
    use super::*;

    #[test]
    fn path_source_with_mmap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"a,b\n1,2\n3,4\n")
            .unwrap();

        let file = parse_path(&path, ReaderOptions::default()).unwrap();
        assert_eq!(file.rows(), 2);
        assert_eq!(file.get(1, 1), Value::Int(4));
        assert!(file.name().ends_with("data.csv"));

        let opts = ReaderOptions::builder().use_mmap(false).build().unwrap();
        let file = parse_path(&path, opts).unwrap();
        assert_eq!(file.rows(), 2);
    }

    #[test]
    fn tsv_extension_presets_tab() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.tsv");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"a\tb\n1\t2\n")
            .unwrap();

        let file = parse_path(&path, ReaderOptions::default()).unwrap();
        assert_eq!(file.names(), ["a", "b"]);
        assert_eq!(file.get(1, 0), Value::Int(2));
    }

    #[test]
    fn reader_source() {
        let cursor = std::io::Cursor::new(b"a\n1\n2\n".to_vec());
        let file = tapecsv::parse_reader(cursor, ReaderOptions::default()).unwrap();
        assert_eq!(file.rows(), 2);
    }

    #[test]
    fn command_source() {
        let mut cmd = std::process::Command::new("printf");
        cmd.arg("a,b\\n1,2\\n");
        let file = File::parse(Source::command(cmd), ReaderOptions::default()).unwrap();
        assert_eq!(file.names(), ["a", "b"]);
        assert_eq!(file.rows(), 1);
    }

    #[test]
    fn missing_path_is_invalid_source() {
        let err = parse_path("/no/such/file.csv", ReaderOptions::default()).unwrap_err();
        assert!(err.to_string().starts_with("invalid source:"));
    }
}

mod round_trip {
    use super::*;

    // Every cell re-parsed from its original bytes must equal the read
    // value, whatever the column's final type ended up being.
    #[test]
    fn values_match_original_fields() {
        let data = "i,f,s,d\n\
                    1,1.5,alpha,2024-01-01\n\
                    2,2.5,beta,2024-01-02\n\
                    3,3.5,gamma,2024-01-03\n";
        let file = parse(data);

        let originals: Vec<Vec<&str>> = data
            .lines()
            .skip(1)
            .map(|l| l.split(',').collect())
            .collect();

        for (row, fields) in originals.iter().enumerate() {
            assert_eq!(file.get(0, row), Value::Int(fields[0].parse().unwrap()));
            assert_eq!(file.get(1, row), Value::Float(fields[1].parse().unwrap()));
            assert_eq!(string_of(file.get(2, row)), fields[2]);
            let Value::Date(days) = file.get(3, row) else { panic!("expected date") };
            assert_eq!(days, 19723 + row as i32);
        }
    }
}
